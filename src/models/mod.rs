mod subject;
mod timetable;

pub use subject::*;
pub use timetable::*;
