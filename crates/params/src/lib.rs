//! Parameter layer: the source algebra, the partitioned data source, and
//! the adapter that binds stable job numbers to parameter records.

pub mod adapter;
pub mod basic;
pub mod combinators;
pub mod data;
pub mod dump;
pub mod error;
pub mod mapping;
pub mod source;

pub use adapter::{AdapterOptions, ParameterAdapter, StartupPrecedence, TrackedParameterAdapter};
pub use basic::{
    CollectSource, ConstSource, CounterSource, InternalSource, RequirementSource, RngSource,
    ValuesSource,
};
pub use combinators::{
    ChainSource, CrossSource, ForwardingSource, RangeSource, RepeatSource, VariationSource,
    ZipSource,
};
pub use data::{DataParameterSource, DataSourceOptions};
pub use dump::DumpSource;
pub use error::ParameterError;
pub use mapping::JobMapping;
pub use source::{NullSource, ParameterSource, JOB_ID_KEY, PARAM_ID_KEY};
