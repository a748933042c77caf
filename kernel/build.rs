fn main() {
    // Only the bare-metal target links with the kernel layout script; host
    // test builds must not see it.
    let target = std::env::var("TARGET").unwrap_or_default();
    if target.starts_with("i686-unknown-none") {
        println!(
            "cargo:rustc-link-search=native={}",
            concat!(env!("CARGO_MANIFEST_DIR"))
        );
        println!("cargo:rustc-link-arg=-Tlinker.ld");
    }
    println!("cargo:rerun-if-changed=linker.ld");
}
