mod builder;
mod coerce;
mod condition;
mod convert;
mod error;
mod expression;
mod modifier;
mod operator;
mod processor;
mod update;

pub use builder::{QueryBuilder, QueryOptions, SelectQuery};
pub use condition::Condition;
pub use convert::{MongoConverter, PassthroughConverter, ValueConverter, WireType};
pub use error::QueryError;
pub use expression::{ConditionExpr, parse as parse_expression};
pub use modifier::Modifier;
pub use processor::QueryProcessor;
