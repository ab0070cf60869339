use std::collections::{BTreeMap, HashSet};

/// Segment marking a virtual collection-set path
pub const SETS_SEGMENT: &str = "__collectionSets";

/// Normalize a relative path: forward slashes, no leading `./` or `/`,
/// no empty segments, no trailing slash
pub fn normalize_path(path: &str) -> String {
    path.trim()
        .replace('\\', "/")
        .split('/')
        .filter(|seg| !seg.is_empty() && *seg != ".")
        .collect::<Vec<_>>()
        .join("/")
}

/// Folder containing `path` ("" at the root)
pub fn parent_folder(path: &str) -> &str {
    match path.rfind('/') {
        Some(i) => &path[..i],
        None => "",
    }
}

/// First segment of `path`
pub fn top_folder(path: &str) -> &str {
    path.split('/').next().unwrap_or("")
}

/// Last segment of `path`
pub fn file_name(path: &str) -> &str {
    match path.rfind('/') {
        Some(i) => &path[i + 1..],
        None => path,
    }
}

/// Whether `path` lies strictly below `folder` ("" contains everything)
pub fn is_under(path: &str, folder: &str) -> bool {
    folder.is_empty()
        || (path.len() > folder.len()
            && path.starts_with(folder)
            && path.as_bytes()[folder.len()] == b'/')
}

/// `folder` itself followed by each ancestor up to the root
pub fn ancestors(folder: &str) -> Vec<&str> {
    let mut out = vec![folder];
    let mut current = folder;
    while !current.is_empty() {
        current = parent_folder(current);
        out.push(current);
    }
    out
}

/// Join a folder and a name
pub fn join(folder: &str, name: &str) -> String {
    if folder.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", folder, name)
    }
}

/// Human title from a filename: extension dropped, `_`/`-` as spaces,
/// each word capitalized (e.g. "jlpt_n5-verbs.json" -> "Jlpt N5 Verbs")
pub fn title_from_filename(name: &str) -> String {
    let stem = name.strip_suffix(".json").unwrap_or(name);
    stem.split(|c: char| c == '_' || c == '-' || c.is_whitespace())
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Virtual key of a collection set
pub fn virtual_key(base_folder: &str, set_id: &str) -> String {
    join(&join(base_folder, SETS_SEGMENT), set_id)
}

/// Split a virtual key into (base folder, set id)
pub fn parse_virtual_key(key: &str) -> Option<(String, String)> {
    let (prefix, set_id) = match key.rfind('/') {
        Some(i) => (&key[..i], &key[i + 1..]),
        None => return None,
    };
    if set_id.is_empty() || file_name(prefix) != SETS_SEGMENT {
        return None;
    }
    Some((parent_folder(prefix).to_string(), set_id.to_string()))
}

#[derive(Debug, Default)]
struct DirNode {
    folders: BTreeMap<String, DirNode>,
    /// Full keys of collection files directly in this folder
    files: Vec<String>,
}

/// Directory tree built once from the manifest; immutable afterwards
#[derive(Debug, Default)]
pub struct PathTree {
    root: DirNode,
    /// Collection files in manifest order
    files: Vec<String>,
    listed: HashSet<String>,
    /// Every fetchable path, reserved files included
    available: HashSet<String>,
}

impl PathTree {
    /// Build from manifest paths; names matching `is_reserved` are made
    /// available but not listed as collections
    pub fn build<F>(paths: &[String], is_reserved: F) -> Self
    where
        F: Fn(&str) -> bool,
    {
        let mut tree = PathTree::default();
        for raw in paths {
            let path = normalize_path(raw);
            if path.is_empty() || !tree.available.insert(path.clone()) {
                continue;
            }
            let mut node = &mut tree.root;
            let folder = parent_folder(&path);
            if !folder.is_empty() {
                for seg in folder.split('/') {
                    node = node.folders.entry(seg.to_string()).or_default();
                }
            }
            // reserved files still make their folder exist
            if is_reserved(file_name(&path)) {
                continue;
            }
            node.files.push(path.clone());
            tree.listed.insert(path.clone());
            tree.files.push(path);
        }
        tree
    }

    fn node(&self, folder: &str) -> Option<&DirNode> {
        let mut node = &self.root;
        if folder.is_empty() {
            return Some(node);
        }
        for seg in folder.split('/') {
            node = node.folders.get(seg)?;
        }
        Some(node)
    }

    /// Whether `path` is a listed collection file
    pub fn contains_file(&self, path: &str) -> bool {
        self.listed.contains(path)
    }

    /// Whether `path` can be fetched at all
    pub fn is_available(&self, path: &str) -> bool {
        self.available.contains(path)
    }

    /// Every collection file in manifest order
    pub fn files(&self) -> &[String] {
        &self.files
    }

    /// Collection files anywhere below `folder`, in manifest order
    pub fn files_under<'a>(&'a self, folder: &'a str) -> impl Iterator<Item = &'a String> + 'a {
        self.files.iter().filter(move |f| is_under(f, folder))
    }

    /// Immediate subfolder names and file keys of `folder`, unsorted
    pub fn children(&self, folder: &str) -> Option<(Vec<&str>, &[String])> {
        let node = self.node(folder)?;
        let folders = node.folders.keys().map(String::as_str).collect();
        Some((folders, &node.files))
    }
}
