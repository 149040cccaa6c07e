pub mod distribution_lists;
pub mod error;
pub mod exchange;
pub mod graph;
pub mod helpdesk;
pub mod identity;
pub mod metrics;
pub mod mock;
pub mod remote;
pub mod sites;
pub mod tickets;
pub mod tokens;

pub use distribution_lists::DistributionListService;
pub use error::DirectoryError;
pub use exchange::{ExchangeClient, MailDirectory};
pub use graph::{GraphClient, GroupDirectory, GroupRole};
pub use helpdesk::{HelpdeskClient, TicketDesk};
pub use identity::IdentityResolver;
pub use metrics::{get_metrics, init_metrics};
pub use remote::{BearerClient, RemoteError};
pub use sites::{SiteService, SiteSettings};
pub use tickets::TicketService;
pub use tokens::AzureTokenSource;
