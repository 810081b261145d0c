//! 内存场景图工具组
//!
//! 宿主开发环境的最小替身：GameObject（带组件列表）与脚本资源。所有操作共享同一个场景，
//! 作为 ToolGroup 一次性注册；结果按约定带 ✅ / ❌ 标记。演示程序与测试使用它驱动完整的
//! 计划 → 执行 → 自愈流程。

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::tools::{Tool, ToolGroup, ToolParams, ToolRegistry, FAILURE_MARKER, SUCCESS_MARKER};

/// 新建 GameObject 自带的组件
const DEFAULT_COMPONENT: &str = "Transform";

#[derive(Debug, Default)]
pub struct SceneGraph {
    objects: BTreeMap<String, Vec<String>>,
    scripts: BTreeSet<String>,
}

impl SceneGraph {
    pub fn contains(&self, name: &str) -> bool {
        self.objects.contains_key(name)
    }

    pub fn components(&self, name: &str) -> Option<&[String]> {
        self.objects.get(name).map(|c| c.as_slice())
    }

    pub fn has_script(&self, name: &str) -> bool {
        self.scripts.contains(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SceneOp {
    CreateGameObject,
    DeleteGameObject,
    FindGameObject,
    ListGameObjects,
    AddComponent,
    GetComponents,
    RequireComponent,
    CreateScript,
    AttachScript,
}

impl SceneOp {
    const ALL: [SceneOp; 9] = [
        SceneOp::CreateGameObject,
        SceneOp::DeleteGameObject,
        SceneOp::FindGameObject,
        SceneOp::ListGameObjects,
        SceneOp::AddComponent,
        SceneOp::GetComponents,
        SceneOp::RequireComponent,
        SceneOp::CreateScript,
        SceneOp::AttachScript,
    ];

    fn name(self) -> &'static str {
        match self {
            SceneOp::CreateGameObject => "create_gameobject",
            SceneOp::DeleteGameObject => "delete_gameobject",
            SceneOp::FindGameObject => "find_gameobject",
            SceneOp::ListGameObjects => "list_gameobjects",
            SceneOp::AddComponent => "add_component",
            SceneOp::GetComponents => "get_components",
            SceneOp::RequireComponent => "require_component",
            SceneOp::CreateScript => "create_script",
            SceneOp::AttachScript => "attach_script",
        }
    }

    fn description(self) -> &'static str {
        match self {
            SceneOp::CreateGameObject => "Create a GameObject. Params: name",
            SceneOp::DeleteGameObject => "Delete a GameObject. Params: name",
            SceneOp::FindGameObject => "Check that a GameObject exists. Params: name",
            SceneOp::ListGameObjects => "List all GameObjects in the scene",
            SceneOp::AddComponent => "Add a component to a GameObject. Params: target, component",
            SceneOp::GetComponents => "List components of a GameObject. Params: target",
            SceneOp::RequireComponent => {
                "Assert a GameObject has a component. Params: target, component"
            }
            SceneOp::CreateScript => "Create a script asset. Params: name",
            SceneOp::AttachScript => "Attach an existing script to a GameObject. Params: target, script",
        }
    }
}

/// 场景工具组：持有共享场景
#[derive(Clone, Default)]
pub struct SceneTools {
    scene: Arc<RwLock<SceneGraph>>,
}

impl SceneTools {
    pub fn new() -> Self {
        Self::default()
    }

    /// 共享场景句柄（测试中直接检查状态）
    pub fn scene(&self) -> Arc<RwLock<SceneGraph>> {
        Arc::clone(&self.scene)
    }

    /// 只含本组操作的注册表
    pub fn registry(&self) -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.register_group(self);
        registry
    }
}

impl ToolGroup for SceneTools {
    fn tools(&self) -> Vec<Arc<dyn Tool>> {
        SceneOp::ALL
            .iter()
            .map(|&op| {
                Arc::new(SceneTool {
                    op,
                    scene: Arc::clone(&self.scene),
                }) as Arc<dyn Tool>
            })
            .collect()
    }
}

struct SceneTool {
    op: SceneOp,
    scene: Arc<RwLock<SceneGraph>>,
}

fn param<'a>(params: &'a ToolParams, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .find_map(|k| params.get(*k))
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
}

fn missing(key: &str) -> String {
    format!("{FAILURE_MARKER} Invalid parameter '{key}': a value is required")
}

fn object_not_found(name: &str) -> String {
    format!("{FAILURE_MARKER} GameObject '{name}' not found")
}

#[async_trait]
impl Tool for SceneTool {
    fn name(&self) -> &str {
        self.op.name()
    }

    fn description(&self) -> &str {
        self.op.description()
    }

    async fn invoke(&self, params: &ToolParams) -> String {
        const TARGET: &[&str] = &["target", "gameobject", "name"];

        match self.op {
            SceneOp::CreateGameObject => {
                let Some(name) = param(params, &["name"]) else {
                    return missing("name");
                };
                let mut scene = self.scene.write().await;
                if scene.contains(name) {
                    return format!("{SUCCESS_MARKER} GameObject '{name}' already exists");
                }
                scene
                    .objects
                    .insert(name.to_string(), vec![DEFAULT_COMPONENT.to_string()]);
                format!("{SUCCESS_MARKER} Created GameObject '{name}'")
            }
            SceneOp::DeleteGameObject => {
                let Some(name) = param(params, &["name"]) else {
                    return missing("name");
                };
                match self.scene.write().await.objects.remove(name) {
                    Some(_) => format!("{SUCCESS_MARKER} Deleted GameObject '{name}'"),
                    None => object_not_found(name),
                }
            }
            SceneOp::FindGameObject => {
                let Some(name) = param(params, &["name"]) else {
                    return missing("name");
                };
                if self.scene.read().await.contains(name) {
                    format!("{SUCCESS_MARKER} Found GameObject '{name}'")
                } else {
                    object_not_found(name)
                }
            }
            SceneOp::ListGameObjects => {
                let scene = self.scene.read().await;
                if scene.objects.is_empty() {
                    format!("{SUCCESS_MARKER} Scene is empty")
                } else {
                    let names: Vec<&str> = scene.objects.keys().map(String::as_str).collect();
                    format!("{SUCCESS_MARKER} GameObjects: {}", names.join(", "))
                }
            }
            SceneOp::AddComponent => {
                let Some(target) = param(params, TARGET) else {
                    return missing("target");
                };
                let Some(component) = param(params, &["component"]) else {
                    return missing("component");
                };
                let mut scene = self.scene.write().await;
                let Some(components) = scene.objects.get_mut(target) else {
                    return object_not_found(target);
                };
                if components.iter().any(|c| c == component) {
                    return format!(
                        "{SUCCESS_MARKER} GameObject '{target}' already has component '{component}'"
                    );
                }
                components.push(component.to_string());
                format!("{SUCCESS_MARKER} Added component '{component}' to GameObject '{target}'")
            }
            SceneOp::GetComponents => {
                let Some(target) = param(params, TARGET) else {
                    return missing("target");
                };
                match self.scene.read().await.components(target) {
                    Some(c) => format!("{SUCCESS_MARKER} Components on '{target}': {}", c.join(", ")),
                    None => object_not_found(target),
                }
            }
            SceneOp::RequireComponent => {
                let Some(target) = param(params, TARGET) else {
                    return missing("target");
                };
                let Some(component) = param(params, &["component"]) else {
                    return missing("component");
                };
                match self.scene.read().await.components(target) {
                    Some(c) if c.iter().any(|x| x == component) => {
                        format!("{SUCCESS_MARKER} GameObject '{target}' has component '{component}'")
                    }
                    Some(_) => format!(
                        "{FAILURE_MARKER} Component '{component}' not found on GameObject '{target}'"
                    ),
                    None => object_not_found(target),
                }
            }
            SceneOp::CreateScript => {
                let Some(name) = param(params, &["name", "script"]) else {
                    return missing("name");
                };
                let name = name.trim_end_matches(".cs");
                self.scene.write().await.scripts.insert(name.to_string());
                format!("{SUCCESS_MARKER} Created script '{name}.cs'")
            }
            SceneOp::AttachScript => {
                let Some(target) = param(params, &["target", "gameobject"]) else {
                    return missing("target");
                };
                let Some(script) = param(params, &["script"]) else {
                    return missing("script");
                };
                let script = script.trim_end_matches(".cs");
                let mut scene = self.scene.write().await;
                if !scene.has_script(script) {
                    return format!("{FAILURE_MARKER} Script '{script}' not found");
                }
                let Some(components) = scene.objects.get_mut(target) else {
                    return object_not_found(target);
                };
                if !components.iter().any(|c| c == script) {
                    components.push(script.to_string());
                }
                format!("{SUCCESS_MARKER} Attached script '{script}' to GameObject '{target}'")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{params, ToolRegistry, ToolSurface};

    fn registry() -> (ToolRegistry, SceneTools) {
        let scene = SceneTools::new();
        let mut registry = ToolRegistry::new();
        registry.register_group(&scene);
        (registry, scene)
    }

    #[tokio::test]
    async fn test_create_and_find() {
        let (r, scene) = registry();
        let out = r.invoke("create_gameobject", &params(&[("name", "Player")])).await;
        assert!(out.starts_with(SUCCESS_MARKER));
        assert!(scene.scene().read().await.contains("Player"));
        let found = r.invoke("find_gameobject", &params(&[("name", "Player")])).await;
        assert!(found.contains("Found"));
    }

    #[tokio::test]
    async fn test_require_component_reports_missing() {
        let (r, _) = registry();
        r.invoke("create_gameobject", &params(&[("name", "Player")])).await;
        let out = r
            .invoke(
                "require_component",
                &params(&[("target", "Player"), ("component", "Rigidbody")]),
            )
            .await;
        assert_eq!(out, "❌ Component 'Rigidbody' not found on GameObject 'Player'");

        r.invoke(
            "add_component",
            &params(&[("target", "Player"), ("component", "Rigidbody")]),
        )
        .await;
        let comps = r.invoke("get_components", &params(&[("target", "Player")])).await;
        assert!(comps.contains("Transform, Rigidbody"));
    }

    #[tokio::test]
    async fn test_attach_script_requires_script_asset() {
        let (r, _) = registry();
        r.invoke("create_gameobject", &params(&[("name", "Timer")])).await;
        let p = params(&[("target", "Timer"), ("script", "Countdown")]);
        assert_eq!(
            r.invoke("attach_script", &p).await,
            "❌ Script 'Countdown' not found"
        );
        r.invoke("create_script", &params(&[("name", "Countdown.cs")])).await;
        assert!(r.invoke("attach_script", &p).await.starts_with(SUCCESS_MARKER));
    }

    #[tokio::test]
    async fn test_missing_parameter() {
        let (r, _) = registry();
        let out = r.invoke("create_gameobject", &ToolParams::new()).await;
        assert!(out.contains("Invalid parameter 'name'"));
    }
}
