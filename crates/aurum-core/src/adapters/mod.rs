//! Provider adapters over the [`HttpClient`](crate::http_client::HttpClient) abstraction.
//!
//! | Adapter | Class | Capabilities |
//! |---------|-------|--------------|
//! | [`EastmoneyAdapter`] | quote | single, batch |
//! | [`SinaAdapter`] | quote | single |
//! | [`FrankfurterAdapter`] | rate | single |
//! | [`ExchangeRateApiAdapter`] | rate | single |
//! | [`ImfAdapter`] | reserve | single, history |

pub mod eastmoney;
pub mod exchange_rate;
pub mod frankfurter;
pub mod imf;
pub mod sina;
pub mod transport;

pub use eastmoney::EastmoneyAdapter;
pub use exchange_rate::ExchangeRateApiAdapter;
pub use frankfurter::FrankfurterAdapter;
pub use imf::ImfAdapter;
pub use sina::SinaAdapter;
pub use transport::{AdapterTransport, TransportSettings};
