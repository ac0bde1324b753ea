//! 模块解析器
//!
//! 用基于配置搜索路径的 [`ModuleIndex`] 替换全局 `require`。每个解释器实例有自己的
//! [`ModuleResolver`]；实例之间除原生库外不共享任何东西，原生库一旦打开便常驻到进程结束。
//!
//! `require(name)` 的查找顺序：
//!
//! 1. 实例自己的 `package.loaded` 表
//! 2. 宿主预加载器
//! 3. 脚本模块（`name.lua`、`name/init.lua`）
//! 4. 原生模块（`luaopen_<name>`，其中 `.` 换成 `_`）

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::{Arc, Mutex, OnceLock};

use libloading::{Library, Symbol};
use mlua::{Lua, MultiValue, Table, Value};

use crate::config::ModulesConfig;
use crate::core::error::{ModuleError, ModuleResult};

/// 索引中模块的来源
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleSource {
    Script(PathBuf),
    Native(PathBuf),
}

impl ModuleSource {
    pub fn path(&self) -> &Path {
        match self {
            ModuleSource::Script(path) | ModuleSource::Native(path) => path,
        }
    }
}

/// 点分模块名 -> 文件，每个解释器实例构建一次
#[derive(Debug, Clone, Default)]
pub struct ModuleIndex {
    modules: HashMap<String, ModuleSource>,
}

impl ModuleIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// 扫描 `config` 描述的搜索路径
    pub fn from_config(config: &ModulesConfig) -> Self {
        let cwd = if config.include_cwd {
            std::env::current_dir().ok()
        } else {
            None
        };

        let mut index = Self::new();
        let roots = search_roots(config.script_path().as_deref(), &config.suffix, cwd.as_deref());
        index.scan(&roots, &config.suffix, ModuleSource::Script);

        if config.native_modules {
            let roots = search_roots(
                config.native_path().as_deref(),
                &config.native_suffix,
                cwd.as_deref(),
            );
            index.scan(&roots, &config.native_suffix, ModuleSource::Native);
        }

        tracing::debug!(target: "loader", modules = index.len(), "Module index built");
        index
    }

    /// 为每个根目录下的所有 `suffix` 文件建立索引
    ///
    /// 根目录按顺序扫描，先定义某个名称的根目录胜出。
    /// 同一根目录内 `name<suffix>` 优先于 `name/init<suffix>`。
    pub fn scan(&mut self, roots: &[PathBuf], suffix: &str, kind: fn(PathBuf) -> ModuleSource) {
        for root in roots {
            let mut found = BTreeMap::new();
            walk(root, root, suffix, &mut found);

            for (name, (path, _)) in found {
                match self.modules.get(&name) {
                    Some(existing) if existing.path() != path.as_path() => {
                        tracing::warn!(
                            target: "loader",
                            module = %name,
                            used = %existing.path().display(),
                            shadowed = %path.display(),
                            "Module shadowed by an earlier search root"
                        );
                    }
                    Some(_) => {}
                    None => {
                        tracing::trace!(target: "loader", module = %name, path = %path.display(), "Indexed");
                        self.modules.insert(name, kind(path));
                    }
                }
            }
        }
    }

    pub fn insert(&mut self, name: impl Into<String>, source: ModuleSource) {
        self.modules.insert(name.into(), source);
    }

    pub fn get(&self, name: &str) -> Option<&ModuleSource> {
        self.modules.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.modules.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.modules.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

/// 把 `;` 分隔的搜索路径转换为扫描根目录
///
/// 去掉 `?<suffix>` 与 `?/init<suffix>` 模板并丢弃相对路径；
/// 重复项保留首次出现的位置，`cwd` 排在最后。
pub fn search_roots(list: Option<&str>, suffix: &str, cwd: Option<&Path>) -> Vec<PathBuf> {
    let init_template = format!("?/init{}", suffix);
    let template = format!("?{}", suffix);

    let mut roots: Vec<PathBuf> = Vec::new();
    let entries = list
        .unwrap_or_default()
        .split(';')
        .map(|entry| entry.replace(&init_template, "").replace(&template, ""))
        .map(PathBuf::from)
        .chain(cwd.map(Path::to_path_buf));

    for root in entries {
        if root.is_absolute() && !roots.contains(&root) {
            roots.push(root);
        }
    }
    roots
}

fn walk(root: &Path, dir: &Path, suffix: &str, found: &mut BTreeMap<String, (PathBuf, bool)>) {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) => {
            tracing::debug!(target: "loader", dir = %dir.display(), error = %err, "Skipping unreadable directory");
            return;
        }
    };

    let mut paths: Vec<_> = entries.filter_map(Result::ok).collect();
    paths.sort_by_key(|entry| entry.file_name());

    for entry in paths {
        let path = entry.path();
        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        if file_type.is_dir() {
            walk(root, &path, suffix, found);
            continue;
        }
        if !path.is_file() {
            continue;
        }
        let Some((name, is_init)) = module_name(root, &path, suffix) else {
            continue;
        };
        match found.get(&name) {
            // 普通文件优先于 init 文件
            Some((_, false)) => {}
            Some((_, true)) if is_init => {}
            _ => {
                found.insert(name, (path, is_init));
            }
        }
    }
}

/// `root/a/b.lua` -> `a.b`，`root/a/b/init.lua` -> `a.b`
fn module_name(root: &Path, path: &Path, suffix: &str) -> Option<(String, bool)> {
    let relative = path.strip_prefix(root).ok()?;
    let file_name = relative.file_name()?.to_str()?;
    let stem = file_name.strip_suffix(suffix)?;

    let mut parts: Vec<String> = relative
        .parent()
        .map(|parent| {
            parent
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect()
        })
        .unwrap_or_default();

    let is_init = stem == "init";
    if !is_init {
        parts.push(stem.to_string());
    }
    if parts.is_empty() || parts.iter().any(String::is_empty) {
        return None;
    }
    Some((parts.join("."), is_init))
}

/// 宿主侧模块加载器，参数为请求的模块名
pub type PreloadFn = Rc<dyn Fn(&Lua, &str) -> mlua::Result<Value>>;

struct ResolverState {
    index: ModuleIndex,
    preload: HashMap<String, PreloadFn>,
    loading: HashSet<String>,
    loaded: Option<Table>,
}

/// 实例级 `require` 实现
#[derive(Clone)]
pub struct ModuleResolver {
    state: Rc<RefCell<ResolverState>>,
}

impl ModuleResolver {
    pub fn new(index: ModuleIndex) -> Self {
        Self {
            state: Rc::new(RefCell::new(ResolverState {
                index,
                preload: HashMap::new(),
                loading: HashSet::new(),
                loaded: None,
            })),
        }
    }

    /// 把本解析器安装为 `lua` 中的 `require`
    pub fn install(&self, lua: &Lua) -> ModuleResult<()> {
        let loaded = package_loaded(lua)?;
        self.state.borrow_mut().loaded = Some(loaded);

        let resolver = self.clone();
        let require = lua
            .create_function(move |lua, name: String| Ok(resolver.require(lua, &name)?))
            .map_err(|source| load_error("require", source))?;
        lua.globals()
            .set("require", require)
            .map_err(|source| load_error("require", source))?;
        lua.set_app_data(self.clone());
        Ok(())
    }

    /// `lua` 中已安装的解析器（如果有）
    pub fn installed(lua: &Lua) -> Option<ModuleResolver> {
        lua.app_data_ref::<ModuleResolver>().map(|resolver| resolver.clone())
    }

    /// 为 `name` 注册宿主加载器
    pub fn preload<F>(&self, name: impl Into<String>, loader: F)
    where
        F: Fn(&Lua, &str) -> mlua::Result<Value> + 'static,
    {
        let name = name.into();
        tracing::debug!(target: "loader", module = %name, "Preloading");
        self.state.borrow_mut().preload.insert(name, Rc::new(loader));
    }

    pub fn is_indexed(&self, name: &str) -> bool {
        self.state.borrow().index.contains(name)
    }

    pub fn is_loaded(&self, lua: &Lua, name: &str) -> ModuleResult<bool> {
        let loaded = self.loaded(lua)?;
        let value: Value = loaded
            .raw_get(name)
            .map_err(|source| load_error(name, source))?;
        Ok(!value.is_nil())
    }

    /// 解析 `name`；每个实例中加载器最多运行一次
    pub fn require(&self, lua: &Lua, name: &str) -> ModuleResult<Value> {
        let loaded = self.loaded(lua)?;
        let cached: Value = loaded
            .raw_get(name)
            .map_err(|source| load_error(name, source))?;
        if !cached.is_nil() {
            return Ok(cached);
        }

        if !self.state.borrow_mut().loading.insert(name.to_string()) {
            return Err(ModuleError::Cycle(name.to_string()));
        }
        let result = self.load(lua, name);
        self.state.borrow_mut().loading.remove(name);

        let value = result?;
        if !value.is_nil() {
            loaded
                .raw_set(name, value.clone())
                .map_err(|source| load_error(name, source))?;
            return Ok(value);
        }

        // 模块体没有返回值时，保留它自己写入 package.loaded 的值
        let stored: Value = loaded
            .raw_get(name)
            .map_err(|source| load_error(name, source))?;
        if !stored.is_nil() {
            return Ok(stored);
        }
        loaded
            .raw_set(name, true)
            .map_err(|source| load_error(name, source))?;
        Ok(Value::Boolean(true))
    }

    /// 从实例的模块缓存中移除 `name`
    pub fn forget(&self, lua: &Lua, name: &str) -> ModuleResult<()> {
        self.loaded(lua)?
            .raw_set(name, Value::Nil)
            .map_err(|source| load_error(name, source))
    }

    fn load(&self, lua: &Lua, name: &str) -> ModuleResult<Value> {
        let preload = self.state.borrow().preload.get(name).cloned();
        if let Some(loader) = preload {
            tracing::trace!(target: "loader", module = name, "Loading preloaded module");
            return loader(lua, name).map_err(|source| load_error(name, source));
        }

        let source = self.state.borrow().index.get(name).cloned();
        match source {
            Some(ModuleSource::Script(path)) => load_script(lua, name, &path),
            Some(ModuleSource::Native(path)) => load_native(lua, name, &path),
            None => Err(ModuleError::NotFound(name.to_string())),
        }
    }

    fn loaded(&self, lua: &Lua) -> ModuleResult<Table> {
        if let Some(loaded) = &self.state.borrow().loaded {
            return Ok(loaded.clone());
        }
        package_loaded(lua)
    }
}

fn package_loaded(lua: &Lua) -> ModuleResult<Table> {
    let package: Option<Table> = lua
        .globals()
        .get("package")
        .map_err(|source| load_error("package", source))?;
    match package {
        Some(package) => package
            .get::<Table>("loaded")
            .map_err(|source| load_error("package", source)),
        None => lua.create_table().map_err(|source| load_error("package", source)),
    }
}

fn load_error(name: &str, source: mlua::Error) -> ModuleError {
    ModuleError::Load {
        name: name.to_string(),
        source,
    }
}

fn load_script(lua: &Lua, name: &str, path: &Path) -> ModuleResult<Value> {
    let source = fs::read_to_string(path).map_err(|source| ModuleError::Io {
        name: name.to_string(),
        path: path.to_path_buf(),
        source,
    })?;
    tracing::debug!(target: "loader", module = name, path = %path.display(), "Loading script module");
    let results = lua
        .load(source)
        .set_name(format!("@{}", path.display()))
        .call::<MultiValue>(name)
        .map_err(|source| load_error(name, source))?;
    Ok(results.into_iter().next().unwrap_or(Value::Nil))
}

type NativeOpen = mlua::lua_CFunction;

static LIBRARIES: OnceLock<Mutex<HashMap<PathBuf, Arc<Library>>>> = OnceLock::new();

/// 每个 `path` 在进程内只打开一次
pub(crate) fn open_library(path: &Path) -> ModuleResult<Arc<Library>> {
    let libraries = LIBRARIES.get_or_init(|| Mutex::new(HashMap::new()));
    let mut libraries = libraries.lock().map_err(|_| ModuleError::Library {
        path: path.to_path_buf(),
        reason: "library table poisoned".to_string(),
    })?;
    if let Some(library) = libraries.get(path) {
        return Ok(library.clone());
    }

    let library = Arc::new(dlopen_now(path)?);
    libraries.insert(path.to_path_buf(), library.clone());
    tracing::info!(target: "loader", path = %path.display(), "Opened native library");
    Ok(library)
}

/// 立即解析全部符号：缺少的 `lua_*` 符号在这里报错，而不是在首次调用时终止进程
#[cfg(unix)]
fn dlopen_now(path: &Path) -> ModuleResult<Library> {
    use libloading::os::unix::{Library as UnixLibrary, RTLD_LOCAL, RTLD_NOW};

    // SAFETY: 原生 Lua 模块除 C 运行时本身外不执行其他初始化
    unsafe { UnixLibrary::open(Some(path), RTLD_NOW | RTLD_LOCAL) }
        .map(Library::from)
        .map_err(|err| ModuleError::Library {
            path: path.to_path_buf(),
            reason: err.to_string(),
        })
}

#[cfg(not(unix))]
fn dlopen_now(path: &Path) -> ModuleResult<Library> {
    // SAFETY: 同 unix 版本
    unsafe { Library::new(path) }.map_err(|err| ModuleError::Library {
        path: path.to_path_buf(),
        reason: err.to_string(),
    })
}

/// `luaopen_` 加上把点换成下划线的模块名
pub fn open_symbol(name: &str) -> String {
    format!("luaopen_{}", name.replace('.', "_"))
}

/// 在 `path` 对应的库中查找模块初始化函数
pub(crate) fn native_initializer(name: &str, path: &Path) -> ModuleResult<NativeOpen> {
    let library = open_library(path)?;
    let symbol = open_symbol(name);
    // SAFETY: 该符号遵循 lua_CFunction 约定；库从不卸载，
    // 函数指针始终有效
    let open: Symbol<NativeOpen> = unsafe { library.get(symbol.as_bytes()) }.map_err(|_| {
        ModuleError::Symbol {
            symbol: symbol.clone(),
            path: path.to_path_buf(),
        }
    })?;
    Ok(*open)
}

fn load_native(lua: &Lua, name: &str, path: &Path) -> ModuleResult<Value> {
    let open = native_initializer(name, path)?;
    tracing::debug!(target: "loader", module = name, path = %path.display(), "Loading native module");
    // SAFETY: 同 `native_initializer`
    let init = unsafe { lua.create_c_function(open) }.map_err(|source| load_error(name, source))?;
    let results = init
        .call::<MultiValue>((name, path.display().to_string()))
        .map_err(|source| load_error(name, source))?;
    Ok(results.into_iter().next().unwrap_or(Value::Nil))
}
