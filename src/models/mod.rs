pub mod appointment;
pub mod business;
pub mod draft;
pub mod hours;
pub mod policy;
pub mod service;
pub mod slot;

pub use appointment::{Appointment, AppointmentStatus};
pub use business::Business;
pub use draft::{ConversationDraft, DayPart, DraftStage, MissingField, PendingAction};
pub use hours::{DateException, WeeklyHours};
pub use policy::BookingPolicy;
pub use service::ServiceItem;
pub use slot::Slot;
