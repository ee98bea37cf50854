use uuid::Uuid;

pub fn new_room_id() -> String {
    Uuid::new_v4().to_string()
}

pub fn new_user_id() -> String {
    Uuid::new_v4().to_string()
}

pub fn new_connection_id() -> String {
    Uuid::new_v4().to_string()
}
