use crate::models::{Actor, Booking, Business};

/// Authorization hook consulted before owner-side transitions.
pub trait AccessPolicy: Send + Sync {
    fn can_manage(&self, actor: &Actor, business: &Business) -> bool;
}

/// Owners manage their own business; the system actor manages everything.
pub struct BusinessOwnerPolicy;

impl AccessPolicy for BusinessOwnerPolicy {
    fn can_manage(&self, actor: &Actor, business: &Business) -> bool {
        match actor {
            Actor::Owner(id) => *id == business.owner_id,
            Actor::System => true,
            Actor::Customer(_) => false,
        }
    }
}

/// Customers act only on their own bookings.
pub fn is_booking_customer(actor: &Actor, booking: &Booking) -> bool {
    matches!(actor, Actor::Customer(phone) if *phone == booking.customer_phone)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn business() -> Business {
        Business {
            id: "b1".to_string(),
            name: "Salon".to_string(),
            owner_id: "owner-1".to_string(),
            owner_phone: None,
            upi_id: None,
            suspended: false,
        }
    }

    #[test]
    fn test_owner_policy() {
        let policy = BusinessOwnerPolicy;
        assert!(policy.can_manage(&Actor::Owner("owner-1".to_string()), &business()));
        assert!(!policy.can_manage(&Actor::Owner("owner-2".to_string()), &business()));
        assert!(!policy.can_manage(&Actor::Customer("+100".to_string()), &business()));
        assert!(policy.can_manage(&Actor::System, &business()));
    }
}
