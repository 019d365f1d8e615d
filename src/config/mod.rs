// Re-export all items from the submodules
mod batch_config;
mod builder;

// Re-export raw configuration types
pub use batch_config::{
    AwsSection,
    BatchConfig,
    HostEntry,
    LoggingSection,
    RepositorySection,
};

// Re-export the job spec builder
pub use builder::{
    build_jobs,
    log_destination,
    resolve_worker_count,
};
