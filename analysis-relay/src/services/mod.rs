pub mod metrics;
pub mod relay;

pub use self::metrics::{get_metrics, init_metrics};
pub use relay::{RelayError, UploadRelay};
