//! `rondo scenarios`

/// Print every built-in scenario with its description
pub fn handle_list() {
    for scenario in rondo_testkit::catalog() {
        println!("{:<20} {}", scenario.name(), scenario.description());
    }
}
