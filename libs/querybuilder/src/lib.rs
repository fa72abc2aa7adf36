//! # Query Builder
//!
//! Compiles the operator-facing filter language into PostgreSQL predicate
//! fragments. The output is interpolated into a `WHERE` clause by the caller;
//! nothing here executes queries.
//!
//! ```
//! let sql = querybuilder::compile(r#"Name ~^ "web" AND /free.Memory.Free > 1024"#).unwrap();
//! assert_eq!(
//!     sql,
//!     "name LIKE 'web%' and (data #>> '{/free,Memory,Free}')::float8 > 1024"
//! );
//! ```

pub mod error;
pub mod filter;
pub mod parser;

pub use error::{FilterError, Result};
pub use filter::{Clause, Comparison, FilterExpression, Literal, StringField, StringOperator};
pub use parser::parse;

/// Parse and render in one step; an empty filter yields an empty string
pub fn compile(input: &str) -> Result<String> {
    Ok(parse(input)?.to_sql())
}
