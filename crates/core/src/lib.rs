pub mod config;
pub mod engine;
pub mod errors;
pub mod normalize;
pub mod rates;
pub mod region;
pub mod sync;

pub use engine::api::{PjmZoneInfo, UtilityProgramData};
pub use engine::delegates::{
    ConnectedSolutionsRequest, ConnectedSolutionsResolver, TableConnectedSolutionsResolver,
    TableTieredResolver, TieredRequest, TieredResolver,
};
pub use engine::index::TieredProgram;
pub use engine::query::{Descriptor, DescriptorField, RateQuery, RateResult};
pub use engine::RateEngine;
pub use errors::{ApplicationError, InterfaceError, ResolutionFailure, StoreError};
pub use normalize::{AliasError, AliasMap};
pub use rates::{BackingStore, FileBackingStore, InMemoryBackingStore, RateBook, SaveOutcome};
pub use region::{Region, RegionMembership};
pub use sync::{match_cell, ProgramMapping, ProgramSync};
