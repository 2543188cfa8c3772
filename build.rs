//! Linker scripts are only needed for the firmware image; host builds
//! (library tests) link normally.

fn main() {
    let target = std::env::var("TARGET").unwrap_or_default();

    if target.starts_with("thumb") {
        println!("cargo:rustc-link-arg-bins=--nmagic");
        println!("cargo:rustc-link-arg-bins=-Tlink.x");
        println!("cargo:rustc-link-arg-bins=-Tdefmt.x");
    }
}
