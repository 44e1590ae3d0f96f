pub mod alarm;
pub mod notification;
pub mod position;
