//! Constraint kinds and the type-batched storage the solver runs on.

pub mod angular_motor;
pub mod angular_servo;
pub mod ball_socket;
pub mod body_references;
pub mod contact;
pub mod grab_servo;
pub mod hinge;
pub mod servo_settings;
pub mod spring_settings;
pub mod swing_limit;
pub mod swivel_hinge;
pub mod twist_limit;
pub mod twist_motor;
pub mod twist_servo;
pub mod type_batch;
pub mod type_processor;

/// Constraint type id assignments. Contact families occupy the low range,
/// indexed by contact count; joint types follow.
pub mod type_ids {
    pub const CONTACT_CONVEX_ONE_BODY_BASE: i32 = 0; // 1..=4 contacts -> 0..=3
    pub const CONTACT_CONVEX_TWO_BODY_BASE: i32 = 4; // 1..=4 contacts -> 4..=7
    pub const CONTACT_NONCONVEX_ONE_BODY_BASE: i32 = 8; // 2..=8 contacts -> 8..=14
    pub const CONTACT_NONCONVEX_TWO_BODY_BASE: i32 = 15; // 2..=8 contacts -> 15..=21
    pub const BALL_SOCKET: i32 = 22;
    pub const HINGE: i32 = 23;
    pub const SWIVEL_HINGE: i32 = 24;
    pub const SWING_LIMIT: i32 = 25;
    pub const TWIST_SERVO: i32 = 26;
    pub const TWIST_LIMIT: i32 = 27;
    pub const TWIST_MOTOR: i32 = 28;
    pub const ONE_BODY_ANGULAR_SERVO: i32 = 29;
    pub const ONE_BODY_ANGULAR_MOTOR: i32 = 30;
    pub const GRAB_SERVO: i32 = 31;
    pub const COUNT: i32 = 32;

    /// Convex contact type id for a (count, two_body) combination.
    #[inline(always)]
    pub const fn convex_contact(contact_count: i32, two_body: bool) -> i32 {
        if two_body {
            CONTACT_CONVEX_TWO_BODY_BASE + contact_count - 1
        } else {
            CONTACT_CONVEX_ONE_BODY_BASE + contact_count - 1
        }
    }

    /// Nonconvex contact type id for a (count, two_body) combination.
    #[inline(always)]
    pub const fn nonconvex_contact(contact_count: i32, two_body: bool) -> i32 {
        if two_body {
            CONTACT_NONCONVEX_TWO_BODY_BASE + contact_count - 2
        } else {
            CONTACT_NONCONVEX_ONE_BODY_BASE + contact_count - 2
        }
    }

    /// Whether a type id belongs to one of the contact families. The pair
    /// cache only tracks contact constraints.
    #[inline(always)]
    pub const fn is_contact_type(type_id: i32) -> bool {
        type_id < BALL_SOCKET
    }
}
