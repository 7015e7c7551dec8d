//! Input tree enumeration.
use crate::error::Result;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Literal-substring ignore list, applied to entry names at every depth.
#[derive(Clone, Debug, Default)]
pub struct IgnoreList(Vec<String>);

impl IgnoreList {
    pub fn new(entries: &[String]) -> Self {
        Self(entries.to_vec())
    }

    pub fn matches(&self, name: &OsStr) -> bool {
        let name = name.to_string_lossy();
        self.0.iter().any(|s| name.contains(s.as_str()))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Node {
    Leaf(PathBuf),
    Directory {
        name: String,
        path: PathBuf,
        children: Vec<Node>,
    },
}

impl Node {
    pub fn name(&self) -> String {
        match self {
            Node::Leaf(p) => file_name(p),
            Node::Directory { name, .. } => name.clone(),
        }
    }
}

#[derive(Debug, Default)]
pub struct Walk {
    /// Children of the root (or the root itself when it is a file).
    pub nodes: Vec<Node>,
    pub ignored: Vec<PathBuf>,
    /// Paths that could not be enumerated; their subtrees are skipped.
    pub errors: Vec<(PathBuf, String)>,
}

/// Every node in the tree has a UTF-8 name; anything else is rejected
/// during the walk.
fn file_name(p: &Path) -> String {
    p.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

fn utf8_name(name: &OsStr) -> bool {
    name.to_str().is_some()
}

const NOT_UTF8: &str = "file name is not valid UTF-8";

/// Walk `root`, following symlinks, sorted by name. Pre-order entries are
/// folded into a tree with a stack of open directories.
pub fn enumerate(root: &Path, ignore: &IgnoreList) -> Result<Walk> {
    let meta = std::fs::metadata(root)?;
    if meta.is_file() {
        let name = root.file_name().unwrap_or_default();
        let mut walk = Walk::default();
        if ignore.matches(name) {
            walk.ignored.push(root.to_path_buf());
        } else if !utf8_name(name) {
            walk.errors.push((root.to_path_buf(), NOT_UTF8.to_string()));
        } else {
            walk.nodes.push(Node::Leaf(root.to_path_buf()));
        }
        return Ok(walk);
    }

    let mut ignored = Vec::new();
    let mut unnamed = Vec::new();
    let mut errors = Vec::new();
    // (name, path, children); index 0 is the root itself
    let mut stack: Vec<(String, PathBuf, Vec<Node>)> =
        vec![(file_name(root), root.to_path_buf(), Vec::new())];

    let entries = WalkDir::new(root)
        .follow_links(true)
        .sort_by_file_name()
        .min_depth(1)
        .into_iter()
        .filter_entry(|e| {
            if ignore.matches(e.file_name()) {
                ignored.push(e.path().to_path_buf());
                false
            } else if !utf8_name(e.file_name()) {
                unnamed.push((e.path().to_path_buf(), NOT_UTF8.to_string()));
                false
            } else {
                true
            }
        });

    for e in entries {
        // dangling links, loops and unreadable directories fail alone
        let e = match e {
            Ok(e) => e,
            Err(err) => {
                let path = err
                    .path()
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| root.to_path_buf());
                errors.push((path, err.to_string()));
                continue;
            }
        };
        close_until(&mut stack, e.depth());
        if e.file_type().is_dir() {
            stack.push((file_name(e.path()), e.path().to_path_buf(), Vec::new()));
        } else if e.file_type().is_file() {
            if let Some(top) = stack.last_mut() {
                top.2.push(Node::Leaf(e.path().to_path_buf()));
            }
        }
        // sockets, fifos and devices are skipped
    }
    close_until(&mut stack, 1);

    errors.extend(unnamed);
    let nodes = stack.pop().map(|(_, _, c)| c).unwrap_or_default();
    Ok(Walk {
        nodes,
        ignored,
        errors,
    })
}

/// Pop directories deeper than `depth` into their parents.
fn close_until(stack: &mut Vec<(String, PathBuf, Vec<Node>)>, depth: usize) {
    while stack.len() > depth {
        let Some((name, path, children)) = stack.pop() else {
            return;
        };
        match stack.last_mut() {
            Some(parent) => parent.2.push(Node::Directory {
                name,
                path,
                children,
            }),
            None => {
                // root: put it back, it is never closed here
                stack.push((name, path, children));
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn names(nodes: &[Node]) -> Vec<String> {
        nodes.iter().map(|n| n.name()).collect()
    }

    #[test]
    fn builds_nested_tree_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("b/inner")).unwrap();
        fs::write(root.join("a.txt"), b"a").unwrap();
        fs::write(root.join("b/c.txt"), b"c").unwrap();
        fs::write(root.join("b/inner/d.txt"), b"d").unwrap();
        fs::write(root.join("z.txt"), b"z").unwrap();

        let w = enumerate(root, &IgnoreList::default()).unwrap();
        assert_eq!(names(&w.nodes), vec!["a.txt", "b", "z.txt"]);
        match &w.nodes[1] {
            Node::Directory { children, .. } => {
                assert_eq!(names(children), vec!["c.txt", "inner"]);
                match &children[1] {
                    Node::Directory { children, .. } => assert_eq!(names(children), vec!["d.txt"]),
                    other => panic!("expected directory, got {other:?}"),
                }
            }
            other => panic!("expected directory, got {other:?}"),
        }
    }

    #[test]
    fn ignore_list_prunes_at_every_level() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("sub")).unwrap();
        fs::write(root.join(".DS_Store"), b"x").unwrap();
        fs::write(root.join("sub/.DS_Store"), b"x").unwrap();
        fs::write(root.join("sub/keep.txt"), b"k").unwrap();

        let ignore = IgnoreList::new(&[".DS_Store".to_string()]);
        let w = enumerate(root, &ignore).unwrap();
        assert_eq!(w.ignored.len(), 2);
        assert_eq!(names(&w.nodes), vec!["sub"]);
        match &w.nodes[0] {
            Node::Directory { children, .. } => assert_eq!(names(children), vec!["keep.txt"]),
            other => panic!("expected directory, got {other:?}"),
        }
    }

    #[test]
    fn file_root_is_single_leaf() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("one.bin");
        fs::write(&p, b"1").unwrap();
        let w = enumerate(&p, &IgnoreList::default()).unwrap();
        assert_eq!(w.nodes, vec![Node::Leaf(p)]);
    }

    #[cfg(unix)]
    #[test]
    fn dangling_link_is_reported_and_siblings_survive() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("good.txt"), b"g").unwrap();
        std::os::unix::fs::symlink("/nonexistent/target", dir.path().join("zz-dangling")).unwrap();

        let w = enumerate(dir.path(), &IgnoreList::default()).unwrap();
        assert_eq!(names(&w.nodes), vec!["good.txt"]);
        assert_eq!(w.errors.len(), 1);
        assert_eq!(w.errors[0].0, dir.path().join("zz-dangling"));
    }

    #[cfg(unix)]
    #[test]
    fn non_utf8_names_are_errors_not_nodes() {
        use std::os::unix::ffi::OsStrExt;

        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("good.txt"), b"g").unwrap();
        let bad = dir.path().join(OsStr::from_bytes(b"bad\xff.txt"));
        fs::write(&bad, b"b").unwrap();
        let bad_dir = dir.path().join(OsStr::from_bytes(b"dir\xfe"));
        fs::create_dir(&bad_dir).unwrap();
        fs::write(bad_dir.join("inner.txt"), b"i").unwrap();

        let w = enumerate(dir.path(), &IgnoreList::default()).unwrap();
        assert_eq!(names(&w.nodes), vec!["good.txt"]);
        let mut failed: Vec<_> = w.errors.iter().map(|(p, _)| p.clone()).collect();
        failed.sort();
        let mut expected = vec![bad, bad_dir];
        expected.sort();
        assert_eq!(failed, expected);
        assert!(w.errors.iter().all(|(_, why)| why == NOT_UTF8));
    }

    #[test]
    fn empty_directories_are_kept() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("empty")).unwrap();
        let w = enumerate(dir.path(), &IgnoreList::default()).unwrap();
        assert_eq!(
            w.nodes,
            vec![Node::Directory {
                name: "empty".into(),
                path: dir.path().join("empty"),
                children: vec![],
            }]
        );
    }
}
