pub mod schema;
pub mod store;

pub use schema::{
    CapTagCharge, EnergyRate, ErsPeriod, MonthlyReserve, OphrRecord, PjmZoneCharge, RateBook,
    TieredTable, YearTable,
};
pub use store::{get_cell, set_cell, BackingStore, FileBackingStore, InMemoryBackingStore, SaveOutcome};
