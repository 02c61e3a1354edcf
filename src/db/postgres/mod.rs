mod subjects;
mod timetables;

pub use subjects::PostgresSubjectRepo;
pub use timetables::PostgresTimetableRepo;
