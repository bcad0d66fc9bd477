pub mod discount;
pub mod event;
pub mod order;
pub mod ticket;
pub mod ticket_type;

pub use discount::{DiscountCode, DiscountType};
pub use event::{EventInfo, EventSettings, EventStatus};
pub use order::{Order, OrderDetails, OrderItem, OrderStatus};
pub use ticket::{Ticket, TicketStatus};
pub use ticket_type::{Availability, TicketType};
