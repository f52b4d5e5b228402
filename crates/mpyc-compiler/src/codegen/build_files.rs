//! Build integration files for a MicroPython user C module

use std::fmt::Write;

/// `micropython.mk` for the make-based ports
pub fn makefile(module: &str, c_name: &str) -> String {
    let upper = c_name.to_uppercase();
    let mut out = String::new();
    writeln!(out, "{}_MOD_DIR := $(USERMOD_DIR)", upper).unwrap();
    writeln!(out, "SRC_USERMOD_C += $({}_MOD_DIR)/{}.c", upper, module).unwrap();
    writeln!(out, "CFLAGS_USERMOD += -I$({}_MOD_DIR)", upper).unwrap();
    out
}

/// `micropython.cmake` for the CMake-based ports
pub fn cmake(module: &str, c_name: &str) -> String {
    let target = format!("usermod_{}", c_name);
    let mut out = String::new();
    writeln!(out, "add_library({} INTERFACE)", target).unwrap();
    writeln!(out).unwrap();
    writeln!(out, "target_sources({} INTERFACE", target).unwrap();
    writeln!(out, "    ${{CMAKE_CURRENT_LIST_DIR}}/{}.c", module).unwrap();
    writeln!(out, ")").unwrap();
    writeln!(out).unwrap();
    writeln!(out, "target_include_directories({} INTERFACE", target).unwrap();
    writeln!(out, "    ${{CMAKE_CURRENT_LIST_DIR}}").unwrap();
    writeln!(out, ")").unwrap();
    writeln!(out).unwrap();
    writeln!(out, "target_link_libraries(usermod INTERFACE {})", target).unwrap();
    out
}
