pub mod measure;
pub mod pagination;

pub use measure::{BlockMeasurer, HeuristicMeasurer};
pub use pagination::{PageLayout, PageSpacer, paginate};
