pub mod aggregator;
pub mod completion;
pub mod dispatcher;
pub mod executor;
pub mod relay;
pub mod summary;

pub use aggregator::{InMemoryLogStore, LogAggregator, LogStateStore, Versioned};
pub use completion::{CompletionSink, JsonFileSink};
pub use dispatcher::{DispatcherBuilder, DispatcherOptions, QueueDispatcher};
pub use executor::WorkerExecutor;
pub use relay::{LogEvent, LogRelay, LogSubscription};
pub use summary::{CampaignSummary, CategoryStatistics, DestinationRow};
