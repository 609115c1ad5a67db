pub mod booking;
pub mod business;
pub mod payment;
pub mod slot;

pub use booking::{Actor, Booking, BookingStatus, CancelledBy, CustomerInfo};
pub use business::Business;
pub use payment::{NewPayment, Payment, PaymentAttempt, PaymentStatus};
pub use slot::{Slot, SlotConfig, SlotStatus};
