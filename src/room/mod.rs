mod registry;
mod state;

pub use registry::{generate_room_id, RoomRegistry};
pub use state::Room;
