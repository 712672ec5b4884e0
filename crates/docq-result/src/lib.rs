mod result;

pub use result::{ResultIter, ResultSet};
