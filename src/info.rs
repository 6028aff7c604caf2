//! General information about the crate and the emulator, surfaced for
//! diagnostics (the panic dump in [`crate::diag`] prints it).

use crate::gen::{COMPILATION_DATE, COMPILATION_TIME, NAME, VERSION};
use crate::util::capitalize;

pub struct Info;

impl Info {
    /// Obtains the name of the emulator.
    pub fn name() -> String {
        capitalize(NAME)
    }

    /// Obtains the name of the emulator in lowercase, useful for file
    /// paths and other cases where capitalization is undesirable.
    pub fn name_lower() -> String {
        String::from(NAME)
    }

    /// Obtains the version of the emulator.
    pub fn version() -> String {
        String::from(VERSION)
    }

    /// Obtains the system this emulator is emulating.
    pub fn system() -> String {
        String::from("Game Boy")
    }

    pub fn compilation_date() -> String {
        String::from(COMPILATION_DATE)
    }

    pub fn compilation_time() -> String {
        String::from(COMPILATION_TIME)
    }
}
