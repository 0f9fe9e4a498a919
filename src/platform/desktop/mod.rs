mod main_loop;

pub use main_loop::start;
