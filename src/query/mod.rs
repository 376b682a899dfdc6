// Submodules for separation of concerns
mod cursor;
pub mod eval;
pub mod translate;
mod types;

pub use cursor::Cursor;
pub use translate::{DuplicateKeys, OperatorPolicy, TranslateOptions};
pub use types::{
    AggregateKey, AggregateKeys, AggregateOperator, DataType, Filter, Filters, GroupKey, GroupKeys,
    Operator, Order, Projection, Range, SortKey, Update, UpdateOperator, Updates, Value,
};
