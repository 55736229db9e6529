//! Convenience macros for plugin development.

/// Builds a [`PluginMetadata`](crate::traits::PluginMetadata).
///
/// # Example
/// ```rust,ignore
/// let metadata = plugin_metadata!(
///     name: "gzip",
///     version: "1.0.0",
///     description: "Compresses uploads",
///     author: "Dev",
///     tags: ["compression", "upload"]
/// );
/// ```
#[macro_export]
macro_rules! plugin_metadata {
    (name: $name:expr, version: $version:expr $(,)?) => {
        $crate::traits::PluginMetadata::new($name, $version)
    };
    (
        name: $name:expr,
        version: $version:expr,
        description: $desc:expr,
        author: $author:expr
        $(, license: $license:expr)?
        $(, tags: [$($tag:expr),* $(,)?])?
        $(,)?
    ) => {{
        let mut metadata = $crate::traits::PluginMetadata::new($name, $version);
        metadata.description = $desc.to_string();
        metadata.author = $author.to_string();
        $( metadata.license = $license.to_string(); )?
        $( metadata.tags = vec![$($tag.to_string()),*]; )?
        metadata
    }};
}

/// Builds [`OperationArgs`](crate::operation::OperationArgs).
///
/// # Example
/// ```rust,ignore
/// let args = operation_args! {
///     "items" => json!([1, 2, 3]),
///     "dry_run" => json!(true),
/// };
/// ```
#[macro_export]
macro_rules! operation_args {
    () => {
        $crate::operation::OperationArgs::new()
    };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut args = $crate::operation::OperationArgs::new();
        $(
            args.insert($key.to_string(), $value);
        )+
        args
    }};
}
