use std::env;

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    // 测试在运行时编译 C 模块，需要知道目标三元组
    if let Ok(target) = env::var("TARGET") {
        println!("cargo:rustc-env=HOSTLUA_TARGET={}", target);
    }

    // 内置的 Lua 是静态链接的；原生模块要从宿主可执行文件里解析 lua_* 符号
    let family = env::var("CARGO_CFG_TARGET_FAMILY").unwrap_or_default();
    if !family.split(',').any(|f| f == "unix") {
        return;
    }
    match env::var("CARGO_CFG_TARGET_OS").as_deref() {
        Ok("macos") | Ok("ios") => println!("cargo:rustc-link-arg=-Wl,-export_dynamic"),
        _ => println!("cargo:rustc-link-arg=-Wl,--export-dynamic"),
    }
}
