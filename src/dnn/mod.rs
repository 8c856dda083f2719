pub mod conv;
pub mod layer;
pub mod regressor;
pub mod relu;
pub mod sequential;

pub use conv::Conv2d;
pub use layer::Layer;
pub use regressor::HeatmapRegressor;
pub use relu::ReLU;
pub use sequential::Sequential;
