fn main() {
    println!("cargo:rerun-if-changed=sdkconfig.defaults");

    // Only the firmware build needs the ESP-IDF environment; host builds
    // (tests, fuzzing) run without it.
    #[cfg(feature = "espidf")]
    embuild::espidf::sysenv::output();
}
