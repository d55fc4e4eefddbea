mod dash;
mod error;
mod hls;
mod single_flight;

pub use dash::{DashPassthroughCache, DashUpstream};
pub use error::PassthroughError;
pub use hls::{HlsPassthroughCache, Upstream};
pub use single_flight::SingleFlight;
