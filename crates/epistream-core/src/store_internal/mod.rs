pub(crate) mod charts;
pub(crate) mod locations;
pub(crate) mod schema;
pub(crate) mod txn;
