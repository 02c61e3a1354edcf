mod common;
mod subjects;
mod timetables;

pub use subjects::SqliteSubjectRepo;
pub use timetables::SqliteTimetableRepo;
