//! 工作区文件访问
//!
//! WorkspaceFs 绑定工作区根目录，所有相对路径先做词法归一化再校验，必须落在根目录下
//! （禁止 `../` 与绝对路径逃逸；目标或其最近的已存在祖先再按 canonicalize 结果校验，防止符号链接逃逸）。

use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use walkdir::WalkDir;

use crate::core::{DeskError, Result};

/// 遍历时跳过的目录名
const IGNORED_DIRS: &[&str] = &["node_modules", "target", "dist", "build"];

/// 文件类型（按扩展名粗分）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Directory,
    Code,
    Markdown,
    Config,
    Image,
    Text,
    Other,
}

impl FileKind {
    fn classify(path: &Path, is_dir: bool) -> Self {
        if is_dir {
            return Self::Directory;
        }
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "rs" | "go" | "ts" | "tsx" | "js" | "jsx" | "vue" | "py" | "java" | "c" | "h" | "cpp" | "swift"
            | "kt" | "sh" => Self::Code,
            "md" | "markdown" => Self::Markdown,
            "json" | "toml" | "yaml" | "yml" | "ini" | "env" => Self::Config,
            "png" | "jpg" | "jpeg" | "gif" | "svg" | "webp" => Self::Image,
            "txt" | "log" | "csv" => Self::Text,
            _ => Self::Other,
        }
    }
}

/// 单个文件/目录信息
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileInfo {
    /// 相对工作区根目录的路径，使用 `/` 分隔
    pub path: String,
    pub name: String,
    pub kind: FileKind,
    pub size: u64,
    pub modified_at: Option<DateTime<Utc>>,
}

/// 沙箱文件访问
#[derive(Debug, Clone)]
pub struct WorkspaceFs {
    root: PathBuf,
}

impl WorkspaceFs {
    pub fn new(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref().to_path_buf();
        let root = root.canonicalize().unwrap_or(root);
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// 解析相对路径，结果必须在根目录下
    pub fn resolve(&self, relative: &str) -> Result<PathBuf> {
        let mut normalized = PathBuf::new();
        for component in Path::new(relative).components() {
            match component {
                Component::Normal(part) => normalized.push(part),
                Component::CurDir => {}
                Component::ParentDir => {
                    if !normalized.pop() {
                        return Err(DeskError::PathEscape(relative.to_string()));
                    }
                }
                Component::RootDir | Component::Prefix(_) => {
                    return Err(DeskError::PathEscape(relative.to_string()));
                }
            }
        }
        let full = self.root.join(normalized);
        self.check_real_path(&full, relative)?;
        Ok(full)
    }

    /// 从目标往上找到第一个存在的路径（含悬空链接），其真实位置必须在根目录下
    fn check_real_path(&self, full: &Path, relative: &str) -> Result<()> {
        for ancestor in full.ancestors().take_while(|a| a.starts_with(&self.root)) {
            if ancestor.symlink_metadata().is_err() {
                continue;
            }
            let real = ancestor
                .canonicalize()
                .map_err(|_| DeskError::PathEscape(relative.to_string()))?;
            if !real.starts_with(&self.root) {
                tracing::warn!(path = %relative, real = %real.display(), "path resolves outside workspace");
                return Err(DeskError::PathEscape(relative.to_string()));
            }
            return Ok(());
        }
        Ok(())
    }

    /// 递归列出文件，跳过隐藏项与依赖/构建目录
    pub fn list_files(&self) -> Result<Vec<FileInfo>> {
        let walker = WalkDir::new(&self.root)
            .min_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| {
                let name = e.file_name().to_string_lossy();
                !name.starts_with('.') && !(e.file_type().is_dir() && IGNORED_DIRS.contains(&&*name))
            });

        let mut files = Vec::new();
        for entry in walker {
            let entry = entry.map_err(std::io::Error::from)?;
            let relative = entry.path().strip_prefix(&self.root).unwrap_or(entry.path());
            let metadata = entry.metadata().ok();
            let is_dir = entry.file_type().is_dir();
            files.push(FileInfo {
                path: relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/"),
                name: entry.file_name().to_string_lossy().to_string(),
                kind: FileKind::classify(entry.path(), is_dir),
                size: if is_dir { 0 } else { metadata.as_ref().map(|m| m.len()).unwrap_or(0) },
                modified_at: metadata.and_then(|m| m.modified().ok()).map(DateTime::<Utc>::from),
            });
        }
        Ok(files)
    }

    pub fn read_file(&self, relative: &str) -> Result<String> {
        let path = self.resolve(relative)?;
        std::fs::read_to_string(&path).map_err(|e| not_found_or_io(e, relative))
    }

    /// 写入文件（覆盖），父目录不存在时自动创建
    pub fn write_file(&self, relative: &str, content: &str) -> Result<()> {
        let path = self.resolve(relative)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, content)?;
        tracing::debug!(path = %relative, bytes = content.len(), "workspace file written");
        Ok(())
    }

    pub fn create_file(&self, relative: &str, content: &str) -> Result<()> {
        self.write_file(relative, content)
    }

    pub fn create_dir(&self, relative: &str) -> Result<()> {
        let path = self.resolve(relative)?;
        std::fs::create_dir_all(&path)?;
        Ok(())
    }

    /// 删除文件或目录（目录递归删除）
    pub fn delete(&self, relative: &str) -> Result<()> {
        let path = self.resolve(relative)?;
        if path == self.root {
            return Err(DeskError::PathEscape(relative.to_string()));
        }
        let metadata = std::fs::metadata(&path).map_err(|e| not_found_or_io(e, relative))?;
        if metadata.is_dir() {
            std::fs::remove_dir_all(&path)?;
        } else {
            std::fs::remove_file(&path)?;
        }
        Ok(())
    }

    /// 原地改名：目标已存在时拒绝，不创建目录
    pub fn rename(&self, from: &str, to: &str) -> Result<()> {
        let src = self.resolve(from)?;
        let dest = self.resolve(to)?;
        if src.symlink_metadata().is_err() {
            return Err(DeskError::NotFound(from.to_string()));
        }
        if dest.symlink_metadata().is_ok() {
            return Err(DeskError::AlreadyExists(to.to_string()));
        }
        std::fs::rename(&src, &dest).map_err(|e| not_found_or_io(e, from))
    }

    /// 复制文件或目录（目录递归复制），目标父目录不存在时自动创建
    ///
    /// 源目录里的符号链接不跟随，直接跳过。
    pub fn copy(&self, from: &str, to: &str) -> Result<()> {
        let src = self.resolve(from)?;
        let dest = self.resolve(to)?;
        let metadata = std::fs::metadata(&src).map_err(|e| not_found_or_io(e, from))?;
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }

        if !metadata.is_dir() {
            std::fs::copy(&src, &dest)?;
            return Ok(());
        }
        if dest.starts_with(&src) {
            return Err(DeskError::PathEscape(to.to_string()));
        }

        let mut copied = 0usize;
        for entry in WalkDir::new(&src).sort_by_file_name() {
            let entry = entry.map_err(std::io::Error::from)?;
            let relative = entry.path().strip_prefix(&src).unwrap_or(entry.path());
            let target = dest.join(relative);
            let file_type = entry.file_type();
            if file_type.is_dir() {
                std::fs::create_dir_all(&target)?;
            } else if file_type.is_file() {
                std::fs::copy(entry.path(), &target)?;
                copied += 1;
            } else {
                tracing::debug!(path = %entry.path().display(), "skipping symlink while copying");
            }
        }
        tracing::debug!(from = %from, to = %to, files = copied, "workspace directory copied");
        Ok(())
    }

    /// 移动文件或目录，目标父目录不存在时自动创建
    pub fn move_path(&self, from: &str, to: &str) -> Result<()> {
        let src = self.resolve(from)?;
        let dest = self.resolve(to)?;
        if src == self.root {
            return Err(DeskError::PathEscape(from.to_string()));
        }
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::rename(&src, &dest).map_err(|e| not_found_or_io(e, from))
    }

    pub fn full_path(&self, relative: &str) -> Result<PathBuf> {
        self.resolve(relative)
    }
}

fn not_found_or_io(e: std::io::Error, relative: &str) -> DeskError {
    if e.kind() == std::io::ErrorKind::NotFound {
        DeskError::NotFound(relative.to_string())
    } else {
        DeskError::Io(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_resolve_rejects_escape() {
        let dir = TempDir::new().unwrap();
        let fs = WorkspaceFs::new(dir.path());
        assert!(matches!(fs.resolve("../outside"), Err(DeskError::PathEscape(_))));
        assert!(matches!(fs.resolve("/etc/passwd"), Err(DeskError::PathEscape(_))));
        assert!(fs.resolve("a/../b.txt").is_ok());
    }

    #[test]
    fn test_write_read_rename_delete() {
        let dir = TempDir::new().unwrap();
        let fs = WorkspaceFs::new(dir.path());
        fs.write_file("src/main.rs", "fn main() {}").unwrap();
        assert_eq!(fs.read_file("src/main.rs").unwrap(), "fn main() {}");

        fs.rename("src/main.rs", "src/lib.rs").unwrap();
        assert!(matches!(fs.read_file("src/main.rs"), Err(DeskError::NotFound(_))));

        fs.delete("src").unwrap();
        assert!(matches!(fs.read_file("src/lib.rs"), Err(DeskError::NotFound(_))));
    }

    #[test]
    fn test_list_files_skips_hidden_and_ignored() {
        let dir = TempDir::new().unwrap();
        let fs = WorkspaceFs::new(dir.path());
        fs.write_file("README.md", "# hi").unwrap();
        fs.write_file("src/app.ts", "export {}").unwrap();
        fs.write_file(".git/HEAD", "ref").unwrap();
        fs.write_file("node_modules/x/index.js", "").unwrap();

        let files = fs.list_files().unwrap();
        let paths: Vec<&str> = files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["README.md", "src", "src/app.ts"]);
        assert_eq!(files[0].kind, FileKind::Markdown);
        assert_eq!(files[1].kind, FileKind::Directory);
        assert_eq!(files[2].kind, FileKind::Code);
        assert_eq!(files[0].size, 4);
    }

    #[test]
    fn test_rename_refuses_existing_target() {
        let dir = TempDir::new().unwrap();
        let fs = WorkspaceFs::new(dir.path());
        fs.write_file("a.txt", "a").unwrap();
        fs.write_file("b.txt", "b").unwrap();
        assert!(matches!(fs.rename("a.txt", "b.txt"), Err(DeskError::AlreadyExists(_))));
        assert!(matches!(fs.rename("missing.txt", "c.txt"), Err(DeskError::NotFound(_))));
        assert_eq!(fs.read_file("b.txt").unwrap(), "b");
    }

    #[test]
    fn test_copy_file_and_directory() {
        let dir = TempDir::new().unwrap();
        let fs = WorkspaceFs::new(dir.path());
        fs.write_file("src/main.rs", "fn main() {}").unwrap();
        fs.write_file("src/util/mod.rs", "pub fn x() {}").unwrap();

        fs.copy("src/main.rs", "backup/main.rs").unwrap();
        assert_eq!(fs.read_file("backup/main.rs").unwrap(), "fn main() {}");

        fs.copy("src", "src_copy").unwrap();
        assert_eq!(fs.read_file("src_copy/main.rs").unwrap(), "fn main() {}");
        assert_eq!(fs.read_file("src_copy/util/mod.rs").unwrap(), "pub fn x() {}");
        // 源保持不变
        assert_eq!(fs.read_file("src/util/mod.rs").unwrap(), "pub fn x() {}");

        assert!(matches!(fs.copy("nope", "x"), Err(DeskError::NotFound(_))));
        assert!(fs.copy("src", "src/inner").is_err());
        assert!(matches!(fs.copy("src", "../outside"), Err(DeskError::PathEscape(_))));
    }

    #[test]
    fn test_move_path_creates_parent_dirs() {
        let dir = TempDir::new().unwrap();
        let fs = WorkspaceFs::new(dir.path());
        fs.write_file("docs/a.md", "# a").unwrap();

        fs.move_path("docs/a.md", "archive/2024/a.md").unwrap();
        assert_eq!(fs.read_file("archive/2024/a.md").unwrap(), "# a");
        assert!(matches!(fs.read_file("docs/a.md"), Err(DeskError::NotFound(_))));

        fs.move_path("archive", "old/archive").unwrap();
        assert_eq!(fs.read_file("old/archive/2024/a.md").unwrap(), "# a");
        assert!(matches!(fs.move_path("missing", "x"), Err(DeskError::NotFound(_))));
        assert!(fs.move_path(".", "elsewhere").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinked_dir_cannot_be_written_through() {
        let dir = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        let root = dir.path().join("ws");
        std::fs::create_dir_all(&root).unwrap();
        std::os::unix::fs::symlink(outside.path(), root.join("link")).unwrap();
        let fs = WorkspaceFs::new(&root);

        assert!(matches!(fs.write_file("link/pwned.txt", "x"), Err(DeskError::PathEscape(_))));
        assert!(matches!(fs.create_dir("link/sub/dir"), Err(DeskError::PathEscape(_))));
        assert!(matches!(fs.resolve("link/a/b/c.txt"), Err(DeskError::PathEscape(_))));
        assert!(!outside.path().join("pwned.txt").exists());
        assert!(!outside.path().join("sub").exists());

        fs.write_file("inside.txt", "ok").unwrap();
        assert!(matches!(fs.move_path("inside.txt", "link/moved.txt"), Err(DeskError::PathEscape(_))));
        assert!(matches!(fs.copy("inside.txt", "link/copied.txt"), Err(DeskError::PathEscape(_))));
        assert!(!outside.path().join("moved.txt").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_dangling_symlink_is_rejected() {
        let dir = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        let target = outside.path().join("not-yet.txt");
        std::os::unix::fs::symlink(&target, dir.path().join("dangling.txt")).unwrap();
        let fs = WorkspaceFs::new(dir.path());

        assert!(matches!(fs.write_file("dangling.txt", "x"), Err(DeskError::PathEscape(_))));
        assert!(!target.exists());
    }

    #[test]
    fn test_delete_root_is_refused() {
        let dir = TempDir::new().unwrap();
        let fs = WorkspaceFs::new(dir.path());
        assert!(fs.delete(".").is_err());
    }
}
