// 构建脚本: 静态链接FFmpeg时补齐系统库
fn main() {
    // 仅在Windows MSVC环境下需要
    #[cfg(all(target_os = "windows", target_env = "msvc"))]
    {
        // libmfx: Intel QSV, oleaut32/vfw32: 设备枚举, secur32: RTSP over TLS
        for lib in ["libmfx", "oleaut32", "vfw32", "secur32"] {
            println!("cargo:rustc-link-lib=dylib={}", lib);
        }
    }
}
