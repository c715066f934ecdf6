mod clock_port;
mod http_port;
mod image_cache_port;
mod image_port;
mod observer_port;
mod publisher_port;
mod resolver_port;

pub use clock_port::{Clock, SystemClock};
pub use http_port::{HttpFetcher, HttpResponse};
pub use image_cache_port::ImageCachePort;
pub use image_port::{ImageDecoder, Transformation};
pub use observer_port::{DownloadObserver, RequestObserver};
pub use publisher_port::{MainThreadPoster, Publication, PublicationKind};
pub use resolver_port::{DataResolver, ResolvedData};
