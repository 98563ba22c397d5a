mod error;

pub mod client;
pub mod connectivity;
pub mod dispatch;

pub use self::client::{ApiClient, HttpApiClient, Method};
pub use self::connectivity::{
    connectivity_channel, ConnectivityHandle, ConnectivityProbe, ConnectivitySnapshot,
    NetworkMonitor, NetworkStatus, ReachabilityProbe,
};
pub use self::dispatch::{
    ActionHandler, Dispatch, DispatchError, DispatchTable, HealthSyncHandler,
    ProfileUpdateHandler, QuestCompleteHandler,
};
pub use self::error::NetworkError;
