use serde::Deserialize;
use tracing::info;
use uuid::Uuid;
use validator::Validate;

use super::OrderEngine;
use crate::error::{AppError, AppResult};
use crate::models::{Ticket, TicketStatus};
use crate::store::TxMode;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRequest {
    pub to_user_id: Uuid,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CheckInRequest {
    #[validate(length(min = 1, max = 128))]
    pub qr_code: String,
}

impl OrderEngine {
    /// Hands a confirmed ticket to another user. The QR token is re-issued so
    /// the previous holder's copy stops working at the gate.
    pub async fn transfer_ticket(
        &self,
        ticket_id: Uuid,
        holder_id: Uuid,
        request: TransferRequest,
    ) -> AppResult<Ticket> {
        if request.to_user_id == holder_id {
            return Err(AppError::bad_request("cannot transfer a ticket to yourself"));
        }

        let ticket = self
            .within_deadline("ticket transfer", async {
                let now = self.clock.now();
                let mut tx = self.store.begin(TxMode::ReadCommitted).await?;
                let mut ticket = tx
                    .lock_ticket(ticket_id)
                    .await?
                    .filter(|t| t.user_id == holder_id)
                    .ok_or_else(|| AppError::not_found(format!("ticket {ticket_id} not found")))?;
                if !ticket.is_transferable() {
                    return Err(AppError::conflict(
                        "only confirmed tickets that have not been used can be transferred",
                    ));
                }

                ticket.original_owner_id = ticket.original_owner_id.or(Some(holder_id));
                ticket.user_id = request.to_user_id;
                ticket.transferred_at = Some(now);
                ticket.qr_code = Some(self.qr.generate(ticket.id));

                tx.save_tickets(std::slice::from_ref(&ticket)).await?;
                tx.commit().await?;
                Ok(ticket)
            })
            .await?;

        info!(
            ticket_id = %ticket_id,
            from = %holder_id,
            to = %request.to_user_id,
            "🎟️ Ticket transferred"
        );
        Ok(ticket)
    }

    /// Gate scan by the event organizer. The token is verified offline
    /// before the database is touched.
    pub async fn check_in(
        &self,
        event_id: Uuid,
        organizer_id: Uuid,
        request: CheckInRequest,
    ) -> AppResult<Ticket> {
        request
            .validate()
            .map_err(|e| AppError::bad_request(e.to_string()))?;
        let code = self
            .qr
            .verify(&request.qr_code)
            .map_err(|e| AppError::bad_request(format!("invalid ticket code: {e}")))?;

        let event = self.event(event_id).await?;
        if event.organizer_id != organizer_id {
            return Err(AppError::forbidden("only the event organizer can check in tickets"));
        }

        let ticket = self
            .within_deadline("check-in", async {
                let now = self.clock.now();
                let mut tx = self.store.begin(TxMode::ReadCommitted).await?;
                let mut ticket = tx
                    .lock_ticket_by_code(&code)
                    .await?
                    .ok_or_else(|| AppError::not_found("no ticket with this code"))?;
                if ticket.event_id != event_id {
                    return Err(AppError::conflict("ticket belongs to another event"));
                }
                if ticket.status != TicketStatus::Confirmed {
                    return Err(AppError::conflict(format!("ticket is {:?}", ticket.status)));
                }
                if let Some(at) = ticket.checked_in_at {
                    return Err(AppError::conflict(format!("ticket already checked in at {at}")));
                }

                ticket.checked_in_at = Some(now);
                tx.save_tickets(std::slice::from_ref(&ticket)).await?;
                tx.commit().await?;
                Ok(ticket)
            })
            .await?;

        info!(ticket_id = %ticket.id, event_id = %event_id, "✅ Ticket checked in");
        Ok(ticket)
    }
}
