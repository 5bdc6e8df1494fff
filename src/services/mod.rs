pub mod coordinator;
pub mod dislocation;
pub mod options_table;
pub mod price_cache;
pub mod pricing;
pub mod realized_vol;
pub mod smile;

pub use coordinator::StreamCoordinator;
pub use dislocation::detect_dislocation;
pub use options_table::OptionsTable;
pub use price_cache::PriceCache;
pub use realized_vol::{analyze_iv_vs_rv, RvSeries, RvStore};
pub use smile::{analyze_smile, build_smiles, is_smile_anomaly};
