pub(crate) mod auth;
pub(crate) mod meta;
pub(crate) mod migrate;
pub(crate) mod output;
pub(crate) mod overlap;
pub(crate) mod serve;
pub(crate) mod shared;
pub(crate) mod stats;
pub(crate) mod sync;
