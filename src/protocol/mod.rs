//! Wire protocol spoken with the management service.
//!
//! | Module     | Role                                                  |
//! |------------|-------------------------------------------------------|
//! | `checkin`  | Registration request body, framing and round trip     |
//! | `dispatch` | Classify and apply inbound payloads                   |
//! | `channels` | MQTT channel names and status message bodies          |

pub mod channels;
pub mod checkin;
pub mod dispatch;
