mod subjects;
mod timetables;

pub use subjects::*;
pub use timetables::*;
