fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    // Build scripts run on the host; only device builds (Xtensa) need the
    // ESP-IDF environment exported to rustc.
    let target = std::env::var("TARGET").unwrap_or_default();
    if target.contains("xtensa") {
        embuild::espidf::sysenv::output();
    }
}
