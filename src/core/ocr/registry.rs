//! 进程级 OCR 句柄：启动时安装一次，之后只读

use super::OcrProvider;
use crate::core::error::PipelineError;
use log::info;
use once_cell::sync::OnceCell;
use std::sync::Arc;

static GLOBAL_OCR: OnceCell<Arc<dyn OcrProvider>> = OnceCell::new();

/// 安装全局 OCR 提供方，重复安装返回配置错误
pub fn install_global_provider(provider: Arc<dyn OcrProvider>) -> Result<(), PipelineError> {
    let name = provider.name().to_string();
    GLOBAL_OCR
        .set(provider)
        .map_err(|_| PipelineError::Config("OCR provider already installed".into()))?;
    info!("✅ OCR provider initialized: {}", name);
    Ok(())
}

pub fn global_provider() -> Option<Arc<dyn OcrProvider>> {
    GLOBAL_OCR.get().cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ocr::ScriptedOcr;

    #[test]
    fn test_install_once() {
        let first = install_global_provider(Arc::new(ScriptedOcr::new()));
        let second = install_global_provider(Arc::new(ScriptedOcr::new()));

        // 同一进程内其他测试可能已安装过，但第二次必然失败
        assert!(first.is_ok() || first.unwrap_err().is_config());
        assert!(second.unwrap_err().is_config());
        assert!(global_provider().is_some());
    }
}
