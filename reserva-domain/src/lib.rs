pub mod availability;
pub mod booking;
pub mod events;
pub mod payment;
pub mod resource;

pub use availability::{AvailabilityResult, DaySnapshot, TimeSlot, UnavailableReason};
pub use booking::{Booking, BookingResult, BookingStatus, CreateBookingRequest};
pub use events::BookingEvent;
pub use payment::{Payment, PaymentMethod, PaymentStatus};
pub use resource::{AvailabilityRule, Resource};
