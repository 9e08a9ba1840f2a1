//! 请求 DTO 定义
//!
//! 字段命名与线上协议保持一致（`cels`、`testCases`）。

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use validator::Validate;
use validation_engine::{
    RegistrationRequest, TestCase, ValidationDefinition, ValidationItem, VariableDecl,
};

/// 注册请求
#[derive(Debug, Deserialize, Validate)]
pub struct RegisterDslRequest {
    #[validate(length(min = 1, message = "validations 不能为空"), nested)]
    pub validations: Vec<ValidationDto>,
}

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct ValidationDto {
    #[validate(length(min = 1, max = 256, message = "校验 ID 长度必须在1-256个字符之间"))]
    pub id: String,
    #[validate(length(min = 1, message = "至少需要一个表达式"))]
    pub cels: Vec<String>,
    #[serde(default)]
    #[validate(nested)]
    pub variables: Vec<VariableDto>,
    #[serde(default, rename = "testCases")]
    pub test_cases: Vec<TestCase>,
}

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct VariableDto {
    #[validate(length(min = 1, message = "变量名不能为空"))]
    pub name: String,
    #[serde(rename = "type")]
    #[validate(length(min = 1, message = "变量类型不能为空"))]
    pub type_name: String,
}

impl From<RegisterDslRequest> for RegistrationRequest {
    fn from(req: RegisterDslRequest) -> Self {
        RegistrationRequest {
            validations: req
                .validations
                .into_iter()
                .map(|v| ValidationDefinition {
                    id: v.id,
                    expressions: v.cels,
                    variables: v
                        .variables
                        .into_iter()
                        .map(|d| VariableDecl::new(d.name, d.type_name))
                        .collect(),
                    test_cases: v.test_cases,
                })
                .collect(),
        }
    }
}

/// 批量校验请求
#[derive(Debug, Deserialize, Validate)]
pub struct CheckRequest {
    #[validate(nested)]
    pub validations: Vec<CheckItemDto>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CheckItemDto {
    #[validate(length(min = 1, message = "校验 ID 不能为空"))]
    pub id: String,
    #[serde(default)]
    pub variables: HashMap<String, Value>,
}

impl CheckRequest {
    pub fn into_items(self) -> Vec<ValidationItem> {
        self.validations
            .into_iter()
            .map(|item| ValidationItem {
                id: item.id,
                variables: item.variables,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_register_request_validation() {
        let req: RegisterDslRequest = serde_json::from_value(json!({
            "validations": [{
                "id": "",
                "cels": ["x > 0"],
                "variables": [{"name": "x", "type": "int"}]
            }]
        }))
        .unwrap();
        assert!(req.validate().is_err());

        let req: RegisterDslRequest = serde_json::from_value(json!({"validations": []})).unwrap();
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_register_request_conversion() {
        let req: RegisterDslRequest = serde_json::from_value(json!({
            "validations": [{
                "id": "item",
                "cels": ["price > 0"],
                "variables": [{"name": "price", "type": "int"}]
            }]
        }))
        .unwrap();
        assert!(req.validate().is_ok());

        let registration = RegistrationRequest::from(req);
        assert_eq!(registration.validations[0].expressions, vec!["price > 0"]);
        assert_eq!(
            registration.validations[0].variables[0],
            VariableDecl::new("price", "int")
        );
    }

    #[test]
    fn test_check_request_nested_validation() {
        let req: CheckRequest = serde_json::from_value(json!({
            "validations": [{"id": "", "variables": {}}]
        }))
        .unwrap();
        assert!(req.validate().is_err());
    }
}
