fn main() {
    println!("cargo:rerun-if-changed=sdkconfig.defaults");

    // Host builds (tests, fuzzing) run without the espidf feature and have
    // no ESP-IDF environment to export.
    #[cfg(feature = "espidf")]
    embuild::espidf::sysenv::output();
}
