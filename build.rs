fn main() {
    println!("cargo:rerun-if-env-changed=DEVLINK_API_KEY");
    println!("cargo:rerun-if-env-changed=DEVLINK_OWNER");
    println!("cargo:rerun-if-env-changed=DEVLINK_UDID");
    println!("cargo:rerun-if-env-changed=DEVLINK_COMMIT_ID");
    println!("cargo:rerun-if-env-changed=DEVLINK_FIRMWARE_VERSION");
    println!("cargo:rerun-if-env-changed=DEVLINK_ENV_SSID");

    // Host builds (tests, fuzzing) carry no ESP-IDF sysenv.
    #[cfg(feature = "espidf")]
    embuild::espidf::sysenv::output();
}
