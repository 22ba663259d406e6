//! Build script for KeyRelay.Macro
//! Embeds Windows resource metadata

fn main() {
    #[cfg(windows)]
    {
        let mut res = winresource::WindowsResource::new();
        res.set("FileDescription", "KeyRelay trigger engine and macro runner");
        res.set("ProductName", "KeyRelay");
        res.set("InternalName", "KeyRelay_Macro");
        res.set("OriginalFilename", "KeyRelay_Macro.exe");

        if let Err(e) = res.compile() {
            println!("cargo:warning=Failed to compile Windows resources: {}", e);
        }
    }
}
