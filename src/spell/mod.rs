//! Spells: manifests, the subprocess wire format, and the runner.

pub mod manifest;
pub mod protocol;
pub mod runner;

pub use manifest::{list_spells, load_manifest, InstalledSpell, SpellManifest};
pub use protocol::{SpellRequest, SpellResult, SpellStatus};
pub use runner::SpellRunner;
