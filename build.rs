fn main() {
    // Inject compile timestamp as version
    // This allows tracking which agent binary is running on a field device
    let version = get_version();
    println!("cargo:rustc-env=BUILD_VERSION={}", version);
}

fn get_version() -> String {
    // Format: YYYY-MM-DDTHH:MM:SSZ
    chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}
