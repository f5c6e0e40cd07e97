pub mod click;
pub mod open;
pub mod unsubscribe;
