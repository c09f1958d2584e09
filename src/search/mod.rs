//! Query construction: the generic query builder and the catalogue of
//! predefined flight queries.

pub mod flights;
pub mod query;
