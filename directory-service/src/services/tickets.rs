use super::error::DirectoryError;
use super::helpdesk::{NewTicket, TicketChanges, TicketDesk, TicketRecord};
use service_core::resilience::{retry, RetryPolicy, THROTTLE_KINDS};
use std::sync::Arc;

pub struct TicketService {
    desk: Arc<dyn TicketDesk>,
}

impl TicketService {
    pub fn new(desk: Arc<dyn TicketDesk>) -> Self {
        Self { desk }
    }

    /// A create that timed out may still have landed, so only throttled
    /// attempts are repeated.
    #[tracing::instrument(skip(self, ticket), fields(subject = %ticket.subject))]
    pub async fn create(&self, ticket: NewTicket) -> Result<TicketRecord, DirectoryError> {
        let policy = RetryPolicy::mutation().retrying(THROTTLE_KINDS);
        let record = retry(&policy, "create_ticket", || self.desk.create_ticket(&ticket)).await?;
        metrics::counter!("tickets_created_total").increment(1);
        Ok(record)
    }

    #[tracing::instrument(skip(self, changes))]
    pub async fn update(&self, ticket_id: u64, changes: TicketChanges) -> Result<TicketRecord, DirectoryError> {
        retry(&RetryPolicy::mutation(), "update_ticket", || {
            self.desk.update_ticket(ticket_id, &changes)
        })
        .await
        .map_err(|e| DirectoryError::from(e).or_not_found(format!("Ticket {}", ticket_id)))
    }
}
