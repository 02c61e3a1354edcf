mod timetables;

pub use timetables::TimetableService;
