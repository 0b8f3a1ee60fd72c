pub mod provider;

pub use provider::{
    InMemoryPriceProvider, JsonFilePriceProvider, PriceBar, PriceHistoryProvider, ProviderError,
};
