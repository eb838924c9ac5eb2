fn main() {
    // onnxruntime local (opcional): solo con la feature `onnx` y ONNXRUNTIME_DIR definido
    println!("cargo:rerun-if-env-changed=ONNXRUNTIME_DIR");
    if std::env::var_os("CARGO_FEATURE_ONNX").is_none() {
        return;
    }

    if let Ok(dir) = std::env::var("ONNXRUNTIME_DIR") {
        println!("cargo:rustc-link-search=native={}/lib", dir);
        println!("cargo:rustc-link-lib=dylib=onnxruntime");
        println!("cargo:rerun-if-changed={}/", dir);
    }
}
