pub mod settings;

pub use settings::{
    CouplingConfig, DomainConfig, DynamicsConfig, PipelineConfig, PrecheckConfig, ProfileConfig,
    RobustnessConfig, StatePolicy, TopicConfig,
};
