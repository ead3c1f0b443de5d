mod common;
mod intake;
mod scheduler;
