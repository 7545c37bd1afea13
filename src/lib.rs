pub mod breakpoint;
pub mod command;
pub mod debugger;
pub mod dwarf;
pub mod elf;
pub mod process;
pub mod registers;
pub mod utils;
