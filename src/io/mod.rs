pub mod dates;
pub mod metadata;
pub mod product;
pub mod raster;

pub use dates::{daily_calendar, read_dates, write_dates};
pub use metadata::{read_zs, SceneMetadata};
pub use product::{find_products, ProductName, SnowProduct};
pub use raster::{RasterReader, RasterWriter};
